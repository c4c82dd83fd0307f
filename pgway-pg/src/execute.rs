//! Statement execution with text-format parameters.
//!
//! Every routine parameter travels as `Option<String>` and every statement
//! is prepared with all-text parameter types; the invocation template's
//! `::type` casts convert server-side. This keeps binding uniform across
//! scalars, arrays (as `{…}` literals) and composites.

use futures_util::{pin_mut, TryStreamExt};
use tokio_postgres::types::Type;
use tokio_postgres::{Client, Row, RowStream};

use crate::error::DbError;

/// Prepare `sql` with all-text parameter types and run it, streaming rows.
pub async fn query_stream(
    client: &Client,
    sql: &str,
    params: &[Option<String>],
) -> Result<RowStream, tokio_postgres::Error> {
    let types = vec![Type::TEXT; params.len()];
    let statement = client.prepare_typed(sql, &types).await?;
    client
        .query_raw(&statement, params.iter().map(|p| p.as_deref()))
        .await
}

/// Run a statement expected to produce at most one row.
pub async fn query_opt(
    client: &Client,
    sql: &str,
    params: &[Option<String>],
) -> Result<Option<Row>, tokio_postgres::Error> {
    let stream = query_stream(client, sql, params).await?;
    pin_mut!(stream);
    stream.try_next().await
}

/// Run a statement for its side effects.
pub async fn execute(
    client: &Client,
    sql: &str,
    params: &[Option<String>],
) -> Result<u64, tokio_postgres::Error> {
    let types = vec![Type::TEXT; params.len()];
    let statement = client.prepare_typed(sql, &types).await?;
    client
        .execute_raw(&statement, params.iter().map(|p| p.as_deref()))
        .await
}

/// Write request-context values into the session before the main statement:
/// one `set_config(key, value, false)` per entry.
pub async fn set_context(
    client: &Client,
    entries: &[(String, String)],
) -> Result<(), DbError> {
    for (key, value) in entries {
        client
            .execute(
                "select set_config($1, $2, false)",
                &[&key.as_str(), &value.as_str()],
            )
            .await
            .map_err(DbError::Execute)?;
    }
    Ok(())
}
