use sqlx::PgPool;

/// Runs queries against the connection pool.
///
/// Each query is a plain struct with a `kanau::processor::Processor` impl
/// for this type, see `entities::payment`.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
