//! The two-table schema (`abstractions`, `triples`) and its migration
//! runner, built on `refinery`-embedded SQL migrations.

use error_stack::{IntoReport, Result, ResultExt};

use crate::error::MigrationError;

refinery::embed_migrations!("migrations");

/// Applies every pending migration in `migrations/` to `client`.
///
/// # Errors
///
/// Returns [`MigrationError`] if a migration fails to apply.
pub(super) async fn run_migrations(client: &mut tokio_postgres::Client) -> Result<(), MigrationError> {
    migrations::runner()
        .run_async(client)
        .await
        .into_report()
        .change_context(MigrationError)?;
    Ok(())
}
