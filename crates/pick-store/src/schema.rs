use anyhow::Result;

const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS symbols (
        symbol TEXT PRIMARY KEY,
        exchange TEXT NOT NULL,
        sector TEXT,
        market_cap REAL,
        beta REAL,
        pe_ratio REAL,
        fundamentals_as_of TEXT,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS daily_bars (
        symbol TEXT NOT NULL,
        date TEXT NOT NULL,
        open REAL NOT NULL,
        high REAL NOT NULL,
        low REAL NOT NULL,
        close REAL NOT NULL,
        volume REAL NOT NULL,
        PRIMARY KEY (symbol, date)
    )",
    "CREATE TABLE IF NOT EXISTS symbol_tiers (
        trade_date TEXT NOT NULL,
        symbol TEXT NOT NULL,
        tier TEXT NOT NULL,
        tier_rank INTEGER NOT NULL,
        active_at TEXT,
        shortlist_at TEXT,
        pick_at TEXT,
        PRIMARY KEY (trade_date, symbol)
    )",
    "CREATE TABLE IF NOT EXISTS shortlist_candidates (
        trade_date TEXT NOT NULL,
        symbol TEXT NOT NULL,
        sector TEXT,
        rank INTEGER NOT NULL,
        prescreen_score REAL NOT NULL,
        prescreen_reasoning TEXT NOT NULL,
        bias TEXT NOT NULL,
        features_json TEXT NOT NULL,
        vision_json TEXT NOT NULL,
        social_json TEXT NOT NULL,
        selected_as_pick INTEGER NOT NULL DEFAULT 0,
        locked INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        enriched_at TEXT,
        PRIMARY KEY (trade_date, symbol)
    )",
    "CREATE TABLE IF NOT EXISTS picks (
        trade_date TEXT NOT NULL,
        symbol TEXT NOT NULL,
        direction TEXT NOT NULL,
        entry_price REAL NOT NULL,
        confidence REAL NOT NULL,
        target_low REAL NOT NULL,
        target_medium REAL NOT NULL,
        target_high REAL NOT NULL,
        stop REAL NOT NULL,
        rationale TEXT NOT NULL,
        strategy TEXT NOT NULL,
        model TEXT NOT NULL,
        created_at TEXT NOT NULL,
        published_at TEXT,
        PRIMARY KEY (trade_date, symbol)
    )",
    "CREATE TABLE IF NOT EXISTS pick_outcomes (
        trade_date TEXT NOT NULL,
        symbol TEXT NOT NULL,
        was_pick INTEGER NOT NULL,
        direction TEXT NOT NULL,
        entry_price REAL NOT NULL,
        target_low REAL NOT NULL,
        target_medium REAL NOT NULL,
        target_high REAL NOT NULL,
        stop REAL NOT NULL,
        status TEXT NOT NULL,
        close_reason TEXT,
        max_gain_pct REAL NOT NULL,
        max_loss_pct REAL NOT NULL,
        days_to_peak INTEGER,
        hit_low INTEGER NOT NULL,
        hit_medium INTEGER NOT NULL,
        hit_high INTEGER NOT NULL,
        stop_hit INTEGER NOT NULL,
        last_return_pct REAL NOT NULL,
        days_tracked INTEGER NOT NULL,
        last_bar_date TEXT,
        closed_at TEXT,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (trade_date, symbol)
    )",
    "CREATE TABLE IF NOT EXISTS weight_sets (
        version INTEGER PRIMARY KEY,
        guidance TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS feature_weights (
        version INTEGER NOT NULL,
        feature TEXT NOT NULL,
        weight REAL NOT NULL,
        PRIMARY KEY (version, feature)
    )",
    "CREATE TABLE IF NOT EXISTS agent_weights (
        version INTEGER NOT NULL,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        value REAL NOT NULL,
        PRIMARY KEY (version, kind, name)
    )",
    "CREATE TABLE IF NOT EXISTS active_weights (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        version INTEGER NOT NULL,
        activated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS arbitrator_decisions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        trade_date TEXT NOT NULL,
        strategy TEXT NOT NULL,
        model TEXT NOT NULL,
        weights_version INTEGER NOT NULL,
        considered_json TEXT NOT NULL,
        factors_json TEXT NOT NULL,
        final_confidence REAL NOT NULL,
        outcome TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS market_conditions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        trade_date TEXT NOT NULL,
        volatility_index REAL NOT NULL,
        index_premarket_change_pct REAL NOT NULL,
        observed_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pipeline_runs (
        trade_date TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        stage TEXT,
        error_kind TEXT,
        message TEXT,
        shortlist_count INTEGER NOT NULL DEFAULT 0,
        pick_count INTEGER NOT NULL DEFAULT 0,
        strategy TEXT,
        weights_version INTEGER,
        started_at TEXT NOT NULL,
        finished_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS learning_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_date TEXT NOT NULL,
        status TEXT NOT NULL,
        weights_version INTEGER,
        samples INTEGER NOT NULL,
        reason TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS agent_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS system_flags (
        name TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_bars_date ON daily_bars(date)",
    "CREATE INDEX IF NOT EXISTS idx_outcomes_status ON pick_outcomes(status)",
    "CREATE INDEX IF NOT EXISTS idx_decisions_date ON arbitrator_decisions(trade_date)",
    "CREATE INDEX IF NOT EXISTS idx_conditions_date ON market_conditions(trade_date)",
];

pub(crate) async fn create_all(pool: &sqlx::AnyPool) -> Result<()> {
    for ddl in TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}
