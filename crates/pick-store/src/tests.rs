#[cfg(test)]
mod pick_store_tests {
    use chrono::{Duration, NaiveDate, Utc};
    use pick_core::{
        ArbitratorDecision, Bar, BarDelta, CloseReason, Direction, Enrichment, FeatureSnapshot, Fundamentals,
        MarketCondition, MarketDataStore, OutcomeLedger, Pick, PickOutcome, PriceTargets, RunStatus,
        ShortlistCandidate, SocialSignal, Stage, SymbolInfo, Tier, TrackingStatus, VisionFlags,
    };

    use crate::{LearningRunRecord, LearningRunStatus, PickStore};

    async fn setup_store() -> PickStore {
        PickStore::connect("sqlite::memory:", 1)
            .await
            .expect("in-memory SQLite")
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn candidate(symbol: &str, rank: u32) -> ShortlistCandidate {
        ShortlistCandidate {
            trade_date: day(),
            symbol: symbol.to_string(),
            sector: Some("Technology".to_string()),
            rank,
            prescreen_score: 0.8,
            prescreen_reasoning: "trend".to_string(),
            bias: Direction::Long,
            features: FeatureSnapshot {
                last_close: 100.0,
                atr_pct: Some(3.0),
                ..Default::default()
            },
            vision: Enrichment::Pending,
            social: Enrichment::Pending,
            selected_as_pick: false,
        }
    }

    fn pick(symbol: &str) -> Pick {
        Pick {
            trade_date: day(),
            symbol: symbol.to_string(),
            direction: Direction::Long,
            entry_price: 100.0,
            confidence: 0.7,
            targets: PriceTargets::from_percentages(Direction::Long, 100.0, [3.0, 6.0, 10.0]),
            stop: 95.0,
            rationale: "breakout with volume".to_string(),
            strategy: "momentum".to_string(),
            model: "fake".to_string(),
        }
    }

    fn decision(outcome: &str) -> ArbitratorDecision {
        ArbitratorDecision {
            trade_date: day(),
            strategy: "momentum".to_string(),
            model: "fake".to_string(),
            weights_version: 0,
            considered: vec!["AAA".to_string(), "BBB".to_string()],
            factors: vec![],
            final_confidence: 0.7,
            outcome: outcome.to_string(),
            created_at: Utc::now(),
        }
    }

    async fn activate(store: &PickStore, symbols: &[&str]) {
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        store.promote_tier(day(), &symbols, Tier::Active).await.unwrap();
    }

    #[tokio::test]
    async fn test_universe_round_trip() {
        let store = setup_store().await;
        let info = SymbolInfo {
            symbol: "AAA".to_string(),
            exchange: "NASDAQ".to_string(),
            sector: Some("Technology".to_string()),
        };
        let fundamentals = Fundamentals {
            market_cap: Some(2.0e9),
            beta: Some(1.1),
            pe_ratio: None,
            as_of: Some(day()),
        };
        store.upsert_symbol(&info, &fundamentals).await.unwrap();

        let deltas: Vec<BarDelta> = (0..5)
            .map(|i| BarDelta {
                symbol: "AAA".to_string(),
                bar: Bar {
                    date: day() - Duration::days(4 - i),
                    open: 10.0,
                    high: 11.0,
                    low: 9.0,
                    close: 10.0 + i as f64,
                    volume: 1000.0,
                },
            })
            .collect();
        assert_eq!(store.upsert_bars(&deltas).await.unwrap(), 5);
        // Upsert on the same key replaces, never duplicates.
        store.upsert_bars(&deltas[4..]).await.unwrap();

        let universe = store.load_universe(day(), 3).await.unwrap();
        assert_eq!(universe.len(), 1);
        assert_eq!(universe[0].bars.len(), 3);
        assert_eq!(universe[0].fundamentals.market_cap, Some(2.0e9));
        assert!(universe[0].bars.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(store.latest_bar_date().await.unwrap(), Some(day()));
    }

    #[tokio::test]
    async fn test_tiers_are_monotonic() {
        let store = setup_store().await;
        activate(&store, &["AAA", "BBB"]).await;

        // Skipping SHORTLIST is refused.
        assert!(store
            .promote_tier(day(), &["AAA".to_string()], Tier::Pick)
            .await
            .is_err());

        store.commit_shortlist(day(), &[candidate("AAA", 1)], &[]).await.unwrap();
        assert_eq!(store.symbol_tier(day(), "AAA").await.unwrap(), Tier::Shortlist);

        // Re-promoting to a lower tier is a no-op, not a regression.
        let promoted = store.promote_tier(day(), &["AAA".to_string()], Tier::Active).await.unwrap();
        assert_eq!(promoted, 0);
        assert_eq!(store.symbol_tier(day(), "AAA").await.unwrap(), Tier::Shortlist);

        let counts = store.tier_counts(day()).await.unwrap();
        assert_eq!(counts[&Tier::Active], 2);
        assert_eq!(counts[&Tier::Shortlist], 1);
        assert_eq!(counts[&Tier::Pick], 0);
    }

    #[tokio::test]
    async fn test_failed_shortlist_commit_leaves_no_rows() {
        let store = setup_store().await;
        activate(&store, &["AAA"]).await;

        // BBB never reached ACTIVE, so the whole commit rolls back.
        let result = store
            .commit_shortlist(day(), &[candidate("AAA", 1), candidate("BBB", 2)], &[])
            .await;
        assert!(result.is_err());
        assert!(store.load_shortlist(day()).await.unwrap().is_empty());
        assert_eq!(store.symbol_tier(day(), "AAA").await.unwrap(), Tier::Active);
    }

    #[tokio::test]
    async fn test_enrichment_and_arbitration_lock() {
        let store = setup_store().await;
        activate(&store, &["AAA", "BBB"]).await;
        store
            .commit_shortlist(day(), &[candidate("AAA", 1), candidate("BBB", 2)], &[])
            .await
            .unwrap();

        let mut shortlist = store.load_shortlist(day()).await.unwrap();
        shortlist[0].vision = Enrichment::Available(VisionFlags {
            breakout: true,
            ..Default::default()
        });
        shortlist[1].social = Enrichment::Unavailable("timeout".to_string());
        assert_eq!(store.save_enrichments(day(), &shortlist).await.unwrap(), 2);

        let reloaded = store.load_shortlist(day()).await.unwrap();
        assert_eq!(reloaded[0].symbol, "AAA");
        assert!(reloaded[0].vision.available().unwrap().breakout);
        assert!(reloaded[1].social.is_unavailable());

        let seeds = vec![
            PickOutcome::new(day(), "AAA".into(), true, Direction::Long, 100.0, pick("AAA").targets, 95.0),
            PickOutcome::new(day(), "BBB".into(), false, Direction::Long, 100.0, pick("BBB").targets, 95.0),
        ];
        store
            .commit_arbitration(day(), &[pick("AAA")], &decision("selected"), &seeds)
            .await
            .unwrap();
        assert!(store.is_arbitrated(day()).await.unwrap());
        assert_eq!(store.symbol_tier(day(), "AAA").await.unwrap(), Tier::Pick);

        // Read-only after arbitration.
        let mut late = reloaded.clone();
        late[0].social = Enrichment::Available(SocialSignal::default());
        assert_eq!(store.save_enrichments(day(), &late).await.unwrap(), 0);

        let shortlist = store.load_shortlist(day()).await.unwrap();
        assert!(shortlist[0].selected_as_pick);
        assert!(!shortlist[1].selected_as_pick);

        // A second arbitration for the same day is refused.
        assert!(store
            .commit_arbitration(day(), &[pick("BBB")], &decision("selected"), &[])
            .await
            .is_err());

        let picks = store.load_picks(day()).await.unwrap();
        assert_eq!(picks, vec![pick("AAA")]);
        assert_eq!(store.mark_published(day()).await.unwrap(), 1);
        assert_eq!(store.mark_published(day()).await.unwrap(), 0);

        let decisions = store.load_decisions(day()).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].considered.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_outcome_is_immutable() {
        let store = setup_store().await;
        activate(&store, &["AAA"]).await;
        store.commit_shortlist(day(), &[candidate("AAA", 1)], &[]).await.unwrap();
        let seed = PickOutcome::new(day(), "AAA".into(), true, Direction::Long, 100.0, pick("AAA").targets, 95.0);
        store
            .commit_arbitration(day(), &[pick("AAA")], &decision("selected"), &[seed.clone()])
            .await
            .unwrap();

        let mut open = store.open_outcomes().await.unwrap();
        assert_eq!(open.len(), 1);
        let mut outcome = open.remove(0);
        outcome.max_gain_pct = 11.0;
        outcome.hit_low = true;
        outcome.hit_medium = true;
        outcome.hit_high = true;
        outcome.status = TrackingStatus::Closed;
        outcome.close_reason = Some(CloseReason::TargetHit);
        outcome.closed_at = Some(Utc::now());
        assert!(store.update_outcome(&outcome).await.unwrap());

        let mut tampered = outcome.clone();
        tampered.max_gain_pct = 50.0;
        assert!(!store.update_outcome(&tampered).await.unwrap());

        let stored = store.load_outcome(day(), "AAA").await.unwrap().unwrap();
        assert_eq!(stored.max_gain_pct, 11.0);
        assert!(stored.is_closed());
        assert!(store.open_outcomes().await.unwrap().is_empty());

        let tracked = store.tracked_candidates(day()).await.unwrap();
        assert_eq!(tracked.len(), 1);
        assert!(tracked[0].outcome.hit_high);
    }

    #[tokio::test]
    async fn test_shortlist_seeds_outcomes_and_picks_replace_them() {
        let store = setup_store().await;
        activate(&store, &["AAA", "BBB"]).await;
        let targets = PriceTargets::from_percentages(Direction::Long, 100.0, [3.0, 6.0, 10.0]);
        let seeds = vec![
            PickOutcome::new(day(), "AAA".into(), false, Direction::Long, 100.0, targets, 97.0),
            PickOutcome::new(day(), "BBB".into(), false, Direction::Long, 100.0, targets, 97.0),
        ];
        store
            .commit_shortlist(day(), &[candidate("AAA", 1), candidate("BBB", 2)], &seeds)
            .await
            .unwrap();

        // Tracked from the moment the shortlist exists, before any arbitration.
        let open = store.open_outcomes().await.unwrap();
        assert_eq!(open.len(), 2);
        assert!(open.iter().all(|o| !o.was_pick));
        assert_eq!(store.tracked_candidates(day()).await.unwrap().len(), 2);

        let mut bbb_seed = seeds[1].clone();
        bbb_seed.stop = 90.0;
        let outcomes = vec![
            PickOutcome::new(day(), "AAA".into(), true, Direction::Long, 100.0, pick("AAA").targets, 95.0),
            bbb_seed,
        ];
        store
            .commit_arbitration(day(), &[pick("AAA")], &decision("selected"), &outcomes)
            .await
            .unwrap();

        let aaa = store.load_outcome(day(), "AAA").await.unwrap().unwrap();
        assert!(aaa.was_pick);
        assert_eq!(aaa.stop, 95.0);
        // The shortlist seed of a non-pick is kept as written.
        let bbb = store.load_outcome(day(), "BBB").await.unwrap().unwrap();
        assert!(!bbb.was_pick);
        assert_eq!(bbb.stop, 97.0);
        assert_eq!(store.load_outcomes(day()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_baseline_weights_before_first_version() {
        let store = setup_store().await;
        let weights = store.load_active_weights().await.unwrap();
        assert_eq!(weights.version, 0);
        assert!(store.active_weights_version().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_records() {
        let store = setup_store().await;
        let mut run = store.start_run(day()).await.unwrap();
        assert_eq!(store.load_run(day()).await.unwrap().unwrap().status, None);

        run.status = Some(RunStatus::Failed {
            stage: Stage::Prescreen,
            kind: "cardinality".to_string(),
            message: "60 of 75".to_string(),
        });
        store.finish_run(&run).await.unwrap();
        let loaded = store.load_run(day()).await.unwrap().unwrap();
        assert_eq!(loaded.status, run.status);
        assert!(loaded.finished_at.is_some());

        // Retrying a failed day reopens the row.
        let mut retry = store.start_run(day()).await.unwrap();
        retry.status = Some(RunStatus::Halted {
            reason: "volatility index 40.0 above 35.0".to_string(),
        });
        store.finish_run(&retry).await.unwrap();
        let loaded = store.load_run(day()).await.unwrap().unwrap();
        assert!(matches!(loaded.status, Some(RunStatus::Halted { .. })));
    }

    #[tokio::test]
    async fn test_market_conditions_latest_wins() {
        let store = setup_store().await;
        let early = MarketCondition {
            trade_date: day(),
            volatility_index: 18.0,
            index_premarket_change_pct: 0.2,
            observed_at: Utc::now() - Duration::hours(2),
        };
        let late = MarketCondition {
            volatility_index: 41.0,
            observed_at: Utc::now(),
            ..early.clone()
        };
        store.record_market_condition(&early).await.unwrap();
        store.record_market_condition(&late).await.unwrap();

        let latest = store.latest_market_condition(day()).await.unwrap().unwrap();
        assert_eq!(latest.volatility_index, 41.0);
        assert!(store
            .latest_market_condition(day() + Duration::days(1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_flags_state_and_learning_log() {
        let store = setup_store().await;
        assert!(store.pipeline_enabled().await.unwrap());
        store.set_flag(crate::FLAG_PIPELINE_ENABLED, false).await.unwrap();
        assert!(!store.pipeline_enabled().await.unwrap());

        store.save_state("last_pipeline_day", "2026-03-10").await.unwrap();
        assert_eq!(
            store.load_state("last_pipeline_day").await.unwrap().as_deref(),
            Some("2026-03-10")
        );
        assert!(store.load_state("missing").await.unwrap().is_none());

        store
            .record_learning_run(&LearningRunRecord {
                run_date: day(),
                status: LearningRunStatus::Rejected,
                weights_version: None,
                samples: 40,
                reason: Some("feature weight exceeds max".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let runs = store.recent_learning_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, LearningRunStatus::Rejected);
    }
}
