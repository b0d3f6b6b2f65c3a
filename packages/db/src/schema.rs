//! Database schema definitions using SurrealQL.

use crate::{Database, Result};

/// Initialize the database schema.
///
/// Idempotent; every process runs it on connect.
pub async fn init_schema(db: &Database) -> Result<()> {
    db.query(JOB_SCHEMA).await?.check()?;
    tracing::debug!("job schema ready");
    Ok(())
}

/// Job table schema.
///
/// The record id is the job id. Timestamps are microseconds since the Unix
/// epoch so comparisons in selection queries are exact integer comparisons.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS job_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS command ON job TYPE string;
DEFINE FIELD IF NOT EXISTS state ON job TYPE string
    ASSERT $value IN ["pending", "processing", "completed", "failed", "dead"];
DEFINE FIELD IF NOT EXISTS attempts ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS max_retries ON job TYPE int DEFAULT 3;
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE int;
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE int;
DEFINE FIELD IF NOT EXISTS locked_by ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS locked_at ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS next_retry_at ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS error ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS output ON job TYPE option<string>;

DEFINE INDEX IF NOT EXISTS job_id_unique ON job FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS job_state ON job FIELDS state;
DEFINE INDEX IF NOT EXISTS job_next_retry ON job FIELDS next_retry_at;
DEFINE INDEX IF NOT EXISTS job_created ON job FIELDS created_at;
DEFINE INDEX IF NOT EXISTS job_locked_at ON job FIELDS locked_at;
"#;
