//! Parameterized SQL against the two-table schema, written against
//! `tokio_postgres::GenericClient` so callers can run them over either a
//! pooled connection or an in-flight transaction.

use error_stack::{IntoReport, Result, ResultExt};
use tokio_postgres::GenericClient;

use crate::{
    abstraction::{AbstractionId, Slot},
    error::BackendIo,
};

fn as_id(raw: i64) -> AbstractionId {
    AbstractionId::new(raw.unsigned_abs())
}

const fn as_raw(id: AbstractionId) -> i64 {
    id.get() as i64
}

pub(super) async fn abstraction_exists(client: &impl GenericClient, id: AbstractionId) -> Result<bool, BackendIo> {
    let row = client
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM abstractions WHERE id = $1)",
            &[&as_raw(id)],
        )
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(row.get(0))
}

pub(super) async fn find_data_id(
    client: &impl GenericClient,
    data: &str,
    format: &str,
) -> Result<Option<AbstractionId>, BackendIo> {
    let row = client
        .query_opt("SELECT id FROM abstractions WHERE data = $1 AND format = $2", &[
            &data, &format,
        ])
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(row.map(|row| as_id(row.get(0))))
}

pub(super) async fn insert_data(
    client: &impl GenericClient,
    data: &str,
    format: &str,
) -> Result<AbstractionId, BackendIo> {
    let row = client
        .query_one(
            "INSERT INTO abstractions (data, format) VALUES ($1, $2) RETURNING id",
            &[&data, &format],
        )
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(as_id(row.get(0)))
}

pub(super) async fn find_constructed_id(
    client: &impl GenericClient,
    canonical_key: &str,
) -> Result<Option<AbstractionId>, BackendIo> {
    let row = client
        .query_opt("SELECT id FROM abstractions WHERE connections = $1", &[
            &canonical_key,
        ])
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(row.map(|row| as_id(row.get(0))))
}

/// Inserts a constructed abstraction row, then its triples (resolving
/// `SELF` to the freshly allocated owner id), then caches the resulting
/// triple ids. Must run inside a transaction: the owner row has to exist
/// before any triple can reference it.
pub(super) async fn insert_constructed(
    transaction: &tokio_postgres::Transaction<'_>,
    canonical_key: &str,
    triples: &[(Slot, Slot, Slot)],
) -> Result<AbstractionId, BackendIo> {
    let row = transaction
        .query_one(
            "INSERT INTO abstractions (connections) VALUES ($1) RETURNING id",
            &[&canonical_key],
        )
        .await
        .into_report()
        .change_context(BackendIo)?;
    let owner = as_id(row.get(0));

    let resolve = |slot: Slot| -> i64 { as_raw(slot.id().unwrap_or(owner)) };

    let mut triple_ids = Vec::with_capacity(triples.len());
    for &(subject, predicate, object) in triples {
        let row = transaction
            .query_one(
                "INSERT INTO triples (subject, predicate, object, owner) VALUES ($1, $2, $3, $4) RETURNING id",
                &[&resolve(subject), &resolve(predicate), &resolve(object), &as_raw(owner)],
            )
            .await
            .into_report()
            .change_context(BackendIo)?;
        triple_ids.push(row.get::<_, i64>(0));
    }

    transaction
        .execute("UPDATE abstractions SET triple_ids = $1 WHERE id = $2", &[
            &triple_ids,
            &as_raw(owner),
        ])
        .await
        .into_report()
        .change_context(BackendIo)?;

    Ok(owner)
}

pub(super) enum StoredKind {
    Data { data: String, format: String },
    Constructed,
}

pub(super) async fn fetch_kind(
    client: &impl GenericClient,
    id: AbstractionId,
) -> Result<Option<StoredKind>, BackendIo> {
    let row = client
        .query_opt("SELECT data, format FROM abstractions WHERE id = $1", &[&as_raw(id)])
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(row.map(|row| match (row.get::<_, Option<String>>(0), row.get::<_, Option<String>>(1)) {
        (Some(data), Some(format)) => StoredKind::Data { data, format },
        _ => StoredKind::Constructed,
    }))
}

/// The triple multiset owned by `owner`, with slots equal to `owner`
/// re-materialised as [`Slot::SelfRef`].
pub(super) async fn fetch_triples_owned_by(
    client: &impl GenericClient,
    owner: AbstractionId,
) -> Result<Vec<(Slot, Slot, Slot)>, BackendIo> {
    let rows = client
        .query(
            "SELECT subject, predicate, object FROM triples WHERE owner = $1",
            &[&as_raw(owner)],
        )
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let slot_of = |raw: i64| {
                let resolved = as_id(raw);
                if resolved == owner {
                    Slot::SelfRef
                } else {
                    Slot::Ref(resolved)
                }
            };
            (slot_of(row.get(0)), slot_of(row.get(1)), slot_of(row.get(2)))
        })
        .collect())
}

/// Every `(subject, predicate, object, owner)` row mentioning `id` anywhere,
/// used by both the safe-delete probe and forced deletion.
pub(super) async fn fetch_mentioning_owners(
    client: &impl GenericClient,
    id: AbstractionId,
) -> Result<Vec<AbstractionId>, BackendIo> {
    let rows = client
        .query(
            "SELECT DISTINCT owner FROM triples WHERE subject = $1 OR predicate = $1 OR object = $1",
            &[&as_raw(id)],
        )
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(rows.into_iter().map(|row| as_id(row.get(0))).collect())
}

/// Whether every triple mentioning `id` is owned by `id` itself (the
/// safe-delete "no external referrer" check).
pub(super) async fn only_self_owned_mentions(client: &impl GenericClient, id: AbstractionId) -> Result<bool, BackendIo> {
    let row = client
        .query_one(
            "SELECT NOT EXISTS (
                SELECT 1 FROM triples
                WHERE (subject = $1 OR predicate = $1 OR object = $1) AND owner != $1
            )",
            &[&as_raw(id)],
        )
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(row.get(0))
}

pub(super) async fn is_remembered(client: &impl GenericClient, id: AbstractionId) -> Result<Option<bool>, BackendIo> {
    let row = client
        .query_opt("SELECT remember FROM abstractions WHERE id = $1", &[&as_raw(id)])
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(row.map(|row| row.get(0)))
}

pub(super) async fn set_remembered(
    client: &impl GenericClient,
    id: AbstractionId,
    value: bool,
) -> Result<bool, BackendIo> {
    let rows = client
        .execute("UPDATE abstractions SET remember = $1 WHERE id = $2", &[
            &value,
            &as_raw(id),
        ])
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(rows > 0)
}

pub(super) async fn all_ids(client: &impl GenericClient) -> Result<Vec<AbstractionId>, BackendIo> {
    let rows = client
        .query("SELECT id FROM abstractions", &[])
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(rows.into_iter().map(|row| as_id(row.get(0))).collect())
}

/// Deletes every abstraction in `ids` in one statement. Their owned triples
/// cascade; subject/predicate/object references are checked only at
/// `COMMIT` (see the migration), so `ids` must be the full closure of
/// mutually-referencing rows being removed together.
pub(super) async fn delete_abstractions(client: &impl GenericClient, ids: &[AbstractionId]) -> Result<(), BackendIo> {
    if ids.is_empty() {
        return Ok(());
    }
    let raw_ids: Vec<i64> = ids.iter().copied().map(as_raw).collect();
    client
        .execute("DELETE FROM abstractions WHERE id = ANY($1)", &[&raw_ids])
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(())
}

pub(super) async fn truncate_all(client: &impl GenericClient) -> Result<(), BackendIo> {
    client
        .batch_execute("TRUNCATE TABLE abstractions RESTART IDENTITY CASCADE")
        .await
        .into_report()
        .change_context(BackendIo)?;
    Ok(())
}
