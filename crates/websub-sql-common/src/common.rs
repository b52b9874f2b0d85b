//! Shared helpers for the SQL drivers

use std::future::Future;

use websub_common::database::Error;

use crate::database::DatabaseExecutor;
use crate::hub::migrations::{Migration, SCHEMA_MAX, SCHEMA_MIN};
use crate::stmt::query;
use crate::{column_as_number, unpack_into};

/// Runs a database operation, logging failures with the statement that
/// produced them.
pub async fn run_db_operation<T, E, F, M>(sql: &str, operation: F, map_err: M) -> Result<T, Error>
where
    F: Future<Output = Result<T, E>>,
    M: FnOnce(E) -> Error,
{
    match operation.await {
        Ok(value) => Ok(value),
        Err(err) => {
            let err = map_err(err);
            if !matches!(err, Error::Duplicate) {
                tracing::error!("Query failed ({}): {}", sql.trim(), err);
            }
            Err(err)
        }
    }
}

fn version_string(version: (u16, u16, u16)) -> String {
    format!("{}.{}.{}", version.0, version.1, version.2)
}

/// Applies unapplied migrations in version order.
///
/// The store keeps its version in `_meta_schema_version`; a version outside
/// the supported window aborts startup rather than running against a schema
/// the code does not understand. Must run inside the caller's transaction.
pub async fn migrate<C>(conn: &C, driver: &str, migrations: &[Migration]) -> Result<(), Error>
where
    C: DatabaseExecutor,
{
    query(
        r#"
        CREATE TABLE IF NOT EXISTS _meta_schema_version (
            major INTEGER NOT NULL,
            minor INTEGER NOT NULL,
            patch INTEGER NOT NULL
        )
        "#,
    )?
    .batch(conn)
    .await?;

    let current = query(r#"SELECT major, minor, patch FROM _meta_schema_version"#)?
        .fetch_one(conn)
        .await?
        .map(|row| {
            unpack_into!(let (major, minor, patch) = row);
            Ok::<_, Error>((
                column_as_number!(major),
                column_as_number!(minor),
                column_as_number!(patch),
            ))
        })
        .transpose()?
        .unwrap_or((0, 0, 0));

    if current != (0, 0, 0) && (current < SCHEMA_MIN || current > SCHEMA_MAX) {
        return Err(Error::UnsupportedSchemaVersion {
            found: version_string(current),
            min: version_string(SCHEMA_MIN),
            max: version_string(SCHEMA_MAX),
        });
    }

    let mut applied = current;
    for (version, sql) in migrations {
        if *version <= current {
            continue;
        }

        tracing::info!(
            "Applying schema migration {} ({})",
            version_string(*version),
            driver
        );
        query(sql)?.batch(conn).await?;
        applied = *version;
    }

    if applied != current {
        query(r#"DELETE FROM _meta_schema_version"#)?
            .execute(conn)
            .await?;
        query(
            r#"
            INSERT INTO _meta_schema_version (major, minor, patch)
            VALUES (:major, :minor, :patch)
            "#,
        )?
        .bind("major", i64::from(applied.0))
        .bind("minor", i64::from(applied.1))
        .bind("patch", i64::from(applied.2))
        .execute(conn)
        .await?;
    }

    Ok(())
}
