use rusqlite::Connection;

/// Initialize the database schema.
///
/// Idempotency keys for post-payment side effects live here as UNIQUE
/// constraints, not just in code: replays hit the constraint, not the
/// application's good intentions.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    // WAL mode: webhook intake writes from concurrent deliveries interleave
    // with checkout reads; synchronous=NORMAL is safe under WAL.
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 1000;
        PRAGMA journal_size_limit = 67108864;

        -- Tenants (coaches - own a catalog and optionally gateway credentials)
        CREATE TABLE IF NOT EXISTS tenants (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Gateway credentials (tenant-scoped or platform default)
        -- access_token is encrypted at rest (see crypto::MasterKey); the
        -- encryption scope is the tenant id, or 'platform' for default rows.
        CREATE TABLE IF NOT EXISTS gateway_credentials (
            id TEXT PRIMARY KEY,
            tenant_id TEXT REFERENCES tenants(id) ON DELETE CASCADE,
            gateway TEXT NOT NULL,
            access_token BLOB NOT NULL,
            sandbox INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        -- One platform-default row per gateway (tenant_id IS NULL)
        CREATE UNIQUE INDEX IF NOT EXISTS idx_gateway_credentials_platform ON gateway_credentials(gateway) WHERE tenant_id IS NULL;
        -- One row per (tenant, gateway)
        CREATE UNIQUE INDEX IF NOT EXISTS idx_gateway_credentials_tenant ON gateway_credentials(tenant_id, gateway) WHERE tenant_id IS NOT NULL;

        -- Plans (recurring subscriptions in a tenant's catalog)
        CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            interval TEXT NOT NULL CHECK (interval IN ('monthly', 'quarterly', 'yearly')),
            price_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'BRL',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_plans_tenant ON plans(tenant_id);

        -- Courses (one-time purchases)
        CREATE TABLE IF NOT EXISTS courses (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            price_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'BRL',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_courses_tenant ON courses(tenant_id);

        -- Manual charges (one-off tenant-raised charges, settled by webhook)
        CREATE TABLE IF NOT EXISTS manual_charges (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
            student_id TEXT NOT NULL,
            description TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'BRL',
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'paid')),
            transaction_id TEXT,
            gateway_payment_id TEXT,
            paid_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_manual_charges_transaction ON manual_charges(transaction_id);
        CREATE INDEX IF NOT EXISTS idx_manual_charges_gateway_payment ON manual_charges(gateway_payment_id);

        -- Content bundle attached to a manual charge (unlocked on settlement)
        CREATE TABLE IF NOT EXISTS manual_charge_courses (
            charge_id TEXT NOT NULL REFERENCES manual_charges(id) ON DELETE CASCADE,
            course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            PRIMARY KEY (charge_id, course_id)
        );

        -- Transactions (the ledger; status is forward-only, enforced in queries)
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
            student_id TEXT NOT NULL,
            item_type TEXT NOT NULL CHECK (item_type IN ('plan', 'course', 'manual_charge')),
            item_id TEXT NOT NULL,
            external_reference TEXT NOT NULL,
            gateway TEXT NOT NULL,
            gateway_preference_id TEXT,
            gateway_payment_id TEXT,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'BRL',
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'paid', 'failed', 'cancelled', 'refunded')),
            payment_method TEXT,
            metadata TEXT,
            paid_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        -- One transaction per gateway payment object
        CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_gateway_payment ON transactions(gateway, gateway_payment_id) WHERE gateway_payment_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_transactions_preference ON transactions(gateway_preference_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_external_ref ON transactions(external_reference);
        CREATE INDEX IF NOT EXISTS idx_transactions_tenant_time ON transactions(tenant_id, created_at DESC);

        -- Webhook events (dedup store; id is the derived webhook identity)
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            gateway TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT,
            attempts INTEGER NOT NULL DEFAULT 1,
            processed INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            processed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_purge ON webhook_events(processed, created_at);

        -- Arrival counters for gateways that omit a stable object id
        CREATE TABLE IF NOT EXISTS webhook_counters (
            gateway TEXT NOT NULL,
            event_type TEXT NOT NULL,
            n INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (gateway, event_type)
        );

        -- Subscriptions (one per paying transaction)
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
            student_id TEXT NOT NULL,
            plan_id TEXT NOT NULL REFERENCES plans(id) ON DELETE CASCADE,
            transaction_id TEXT NOT NULL,
            start_date INTEGER NOT NULL,
            end_date INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(transaction_id)
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_student ON subscriptions(student_id);

        -- Course unlocks (access grants; re-grants are no-ops)
        CREATE TABLE IF NOT EXISTS course_unlocks (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            transaction_id TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(student_id, course_id)
        );

        -- Loyalty point awards (one per student/activity/reference)
        CREATE TABLE IF NOT EXISTS point_awards (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            activity TEXT NOT NULL,
            reference_id TEXT NOT NULL,
            points INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(student_id, activity, reference_id)
        );
        CREATE INDEX IF NOT EXISTS idx_point_awards_student ON point_awards(student_id);
        "#,
    )?;
    Ok(())
}
