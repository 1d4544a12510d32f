//! ScyllaDB / Cassandra storage backend.
//!
//! One prepared statement per schema operation; every call site binds
//! typed values and reads typed rows. Driver failures surface as
//! `QueueError::Storage`.

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use scylla::frame::value::{Counter, CqlTimeuuid};
use scylla::prepared_statement::PreparedStatement;
use scylla::{Session, SessionBuilder};
use tracing::info;
use uuid::Uuid;

use crate::appconfig::StorageConfig;
use crate::error::{QueueError, QueueResult};
use crate::shard::{CounterKey, Shard, ShardKind};
use crate::store::rows::{
    AuditAction, AuditLogRow, AuditStatus, MessageData, QueueMessageRow, QueueRow,
};
use crate::store::schema;
use crate::store::traits::StorageBackend;

pub struct ScyllaStore {
    session: Arc<Session>,
    stmts: Statements,
}

struct Statements {
    insert_queue: PreparedStatement,
    select_queue: PreparedStatement,
    delete_queue: PreparedStatement,

    insert_shard: PreparedStatement,
    list_shards: PreparedStatement,
    delete_shards: PreparedStatement,

    insert_available: PreparedStatement,
    insert_inflight: PreparedStatement,
    select_available: PreparedStatement,
    select_inflight: PreparedStatement,
    delete_available: PreparedStatement,
    delete_inflight: PreparedStatement,
    scan_available: PreparedStatement,
    scan_inflight: PreparedStatement,
    scan_available_after: PreparedStatement,
    scan_inflight_after: PreparedStatement,
    delete_available_shard: PreparedStatement,
    delete_inflight_shard: PreparedStatement,

    insert_body: PreparedStatement,
    select_body: PreparedStatement,
    delete_body: PreparedStatement,
    scan_bodies: PreparedStatement,
    scan_bodies_after: PreparedStatement,

    update_counter: PreparedStatement,
    select_counter: PreparedStatement,
    delete_counters: PreparedStatement,

    insert_audit: PreparedStatement,
    select_audit: PreparedStatement,
}

impl Statements {
    async fn prepare(session: &Session) -> QueueResult<Self> {
        async fn ps(session: &Session, cql: &str) -> QueueResult<PreparedStatement> {
            session.prepare(cql).await.map_err(QueueError::storage)
        }

        Ok(Statements {
            insert_queue: ps(session, schema::INSERT_QUEUE).await?,
            select_queue: ps(session, schema::SELECT_QUEUE).await?,
            delete_queue: ps(session, schema::DELETE_QUEUE).await?,

            insert_shard: ps(session, schema::INSERT_SHARD).await?,
            list_shards: ps(session, schema::LIST_SHARDS).await?,
            delete_shards: ps(session, schema::DELETE_SHARDS).await?,

            insert_available: ps(session, schema::INSERT_AVAILABLE).await?,
            insert_inflight: ps(session, schema::INSERT_INFLIGHT).await?,
            select_available: ps(session, schema::SELECT_AVAILABLE).await?,
            select_inflight: ps(session, schema::SELECT_INFLIGHT).await?,
            delete_available: ps(session, schema::DELETE_AVAILABLE).await?,
            delete_inflight: ps(session, schema::DELETE_INFLIGHT).await?,
            scan_available: ps(session, schema::SCAN_AVAILABLE).await?,
            scan_inflight: ps(session, schema::SCAN_INFLIGHT).await?,
            scan_available_after: ps(session, schema::SCAN_AVAILABLE_AFTER).await?,
            scan_inflight_after: ps(session, schema::SCAN_INFLIGHT_AFTER).await?,
            delete_available_shard: ps(session, schema::DELETE_AVAILABLE_SHARD).await?,
            delete_inflight_shard: ps(session, schema::DELETE_INFLIGHT_SHARD).await?,

            insert_body: ps(session, schema::INSERT_BODY).await?,
            select_body: ps(session, schema::SELECT_BODY).await?,
            delete_body: ps(session, schema::DELETE_BODY).await?,
            scan_bodies: ps(session, schema::SCAN_BODIES).await?,
            scan_bodies_after: ps(session, schema::SCAN_BODIES_AFTER).await?,

            update_counter: ps(session, schema::UPDATE_COUNTER).await?,
            select_counter: ps(session, schema::SELECT_COUNTER).await?,
            delete_counters: ps(session, schema::DELETE_COUNTERS).await?,

            insert_audit: ps(session, schema::INSERT_AUDIT).await?,
            select_audit: ps(session, schema::SELECT_AUDIT).await?,
        })
    }
}

impl ScyllaStore {
    /// Build a session, bootstrap keyspace + tables, prepare statements.
    pub async fn connect(cfg: &StorageConfig) -> QueueResult<Self> {
        let mut builder = SessionBuilder::new();
        for host in &cfg.hosts {
            builder = builder.known_node(host);
        }
        if let (Some(user_env), Some(pass_env)) = (&cfg.username_env, &cfg.password_env) {
            let user = env::var(user_env).map_err(|_| {
                QueueError::InvalidConfig(format!("environment variable '{user_env}' is not set"))
            })?;
            let pass = env::var(pass_env).map_err(|_| {
                QueueError::InvalidConfig(format!("environment variable '{pass_env}' is not set"))
            })?;
            builder = builder.user(user, pass);
        }
        let session = builder.build().await.map_err(QueueError::storage)?;
        info!(hosts = ?cfg.hosts, "connection pool to the storage cluster ready");

        session
            .query(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
                     {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
                    cfg.keyspace, cfg.replication_factor
                ),
                (),
            )
            .await
            .map_err(QueueError::storage)?;
        session
            .use_keyspace(&cfg.keyspace, false)
            .await
            .map_err(QueueError::storage)?;
        for ddl in schema::DDL {
            session.query(*ddl, ()).await.map_err(QueueError::storage)?;
        }
        info!(keyspace = %cfg.keyspace, "storage schema ready");

        let stmts = Statements::prepare(&session).await?;
        Ok(ScyllaStore {
            session: Arc::new(session),
            stmts,
        })
    }

    fn pointer_stmt(&self, kind: ShardKind, op: PointerOp) -> &PreparedStatement {
        match (kind, op) {
            (ShardKind::Default, PointerOp::Insert) => &self.stmts.insert_available,
            (ShardKind::Default, PointerOp::Select) => &self.stmts.select_available,
            (ShardKind::Default, PointerOp::Delete) => &self.stmts.delete_available,
            (ShardKind::Default, PointerOp::Scan) => &self.stmts.scan_available,
            (ShardKind::Default, PointerOp::ScanAfter) => &self.stmts.scan_available_after,
            (ShardKind::Default, PointerOp::DeleteShard) => &self.stmts.delete_available_shard,
            (ShardKind::Inflight, PointerOp::Insert) => &self.stmts.insert_inflight,
            (ShardKind::Inflight, PointerOp::Select) => &self.stmts.select_inflight,
            (ShardKind::Inflight, PointerOp::Delete) => &self.stmts.delete_inflight,
            (ShardKind::Inflight, PointerOp::Scan) => &self.stmts.scan_inflight,
            (ShardKind::Inflight, PointerOp::ScanAfter) => &self.stmts.scan_inflight_after,
            (ShardKind::Inflight, PointerOp::DeleteShard) => &self.stmts.delete_inflight_shard,
        }
    }
}

#[derive(Clone, Copy)]
enum PointerOp {
    Insert,
    Select,
    Delete,
    Scan,
    ScanAfter,
    DeleteShard,
}

fn parse_audit_action(s: &str) -> QueueResult<AuditAction> {
    AuditAction::from_str(s)
        .ok_or_else(|| QueueError::Storage(format!("unknown audit action '{s}'")))
}

fn parse_audit_status(s: &str) -> QueueResult<AuditStatus> {
    AuditStatus::from_str(s)
        .ok_or_else(|| QueueError::Storage(format!("unknown audit status '{s}'")))
}

#[async_trait]
impl StorageBackend for ScyllaStore {
    async fn insert_queue(&self, row: &QueueRow) -> QueueResult<bool> {
        let existed = self.select_queue(&row.name).await?.is_some();
        self.session
            .execute(
                &self.stmts.insert_queue,
                (
                    row.name.as_str(),
                    row.default_region.as_str(),
                    row.regions.clone(),
                    row.inflight_timeout_ms,
                    row.delivery_delay_ms,
                    row.created_at,
                ),
            )
            .await
            .map_err(QueueError::storage)?;
        Ok(!existed)
    }

    async fn select_queue(&self, name: &str) -> QueueResult<Option<QueueRow>> {
        let row = self
            .session
            .execute(&self.stmts.select_queue, (name,))
            .await
            .map_err(QueueError::storage)?
            .maybe_first_row_typed::<(String, String, Vec<String>, i64, i64, i64)>()
            .map_err(QueueError::storage)?;
        Ok(row.map(
            |(name, default_region, regions, inflight_timeout_ms, delivery_delay_ms, created_at)| {
                QueueRow {
                    name,
                    default_region,
                    regions,
                    inflight_timeout_ms,
                    delivery_delay_ms,
                    created_at,
                }
            },
        ))
    }

    async fn select_queues(&self) -> QueueResult<Vec<QueueRow>> {
        self.session
            .query(schema::SELECT_QUEUES, ())
            .await
            .map_err(QueueError::storage)?
            .rows_typed_or_empty::<(String, String, Vec<String>, i64, i64, i64)>()
            .map(|row| {
                row.map(
                    |(
                        name,
                        default_region,
                        regions,
                        inflight_timeout_ms,
                        delivery_delay_ms,
                        created_at,
                    )| QueueRow {
                        name,
                        default_region,
                        regions,
                        inflight_timeout_ms,
                        delivery_delay_ms,
                        created_at,
                    },
                )
                .map_err(QueueError::storage)
            })
            .collect()
    }

    async fn delete_queue(&self, name: &str) -> QueueResult<()> {
        self.session
            .execute(&self.stmts.delete_queue, (name,))
            .await
            .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn insert_shard(&self, shard: &Shard) -> QueueResult<()> {
        self.session
            .execute(
                &self.stmts.insert_shard,
                (
                    shard.queue.as_str(),
                    shard.region.as_str(),
                    shard.kind.as_str(),
                    CqlTimeuuid::from(shard.pointer),
                    shard.shard_id,
                ),
            )
            .await
            .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn list_shards(
        &self,
        queue: &str,
        region: &str,
        kind: ShardKind,
    ) -> QueueResult<Vec<Shard>> {
        self.session
            .execute(&self.stmts.list_shards, (queue, region, kind.as_str()))
            .await
            .map_err(QueueError::storage)?
            .rows_typed_or_empty::<(CqlTimeuuid, i64)>()
            .map(|row| {
                row.map(|(pointer, shard_id)| Shard {
                    queue: queue.to_string(),
                    region: region.to_string(),
                    kind,
                    shard_id,
                    pointer: Uuid::from(pointer),
                })
                .map_err(QueueError::storage)
            })
            .collect()
    }

    async fn delete_shards(&self, queue: &str, region: &str) -> QueueResult<()> {
        self.session
            .execute(&self.stmts.delete_shards, (queue, region))
            .await
            .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn insert_pointer(&self, kind: ShardKind, row: &QueueMessageRow) -> QueueResult<()> {
        self.session
            .execute(
                self.pointer_stmt(kind, PointerOp::Insert),
                (
                    row.queue.as_str(),
                    row.region.as_str(),
                    row.shard_id,
                    CqlTimeuuid::from(row.queue_message_id),
                    row.message_id,
                    row.queued_at,
                    row.inflight_at,
                ),
            )
            .await
            .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn select_pointer(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
        queue_message_id: Uuid,
    ) -> QueueResult<Option<QueueMessageRow>> {
        let row = self
            .session
            .execute(
                self.pointer_stmt(kind, PointerOp::Select),
                (queue, region, shard_id, CqlTimeuuid::from(queue_message_id)),
            )
            .await
            .map_err(QueueError::storage)?
            .maybe_first_row_typed::<(Uuid, i64, Option<i64>)>()
            .map_err(QueueError::storage)?;
        Ok(row.map(|(message_id, queued_at, inflight_at)| QueueMessageRow {
            queue: queue.to_string(),
            region: region.to_string(),
            shard_id,
            queue_message_id,
            message_id,
            queued_at,
            inflight_at,
        }))
    }

    async fn delete_pointer(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
        queue_message_id: Uuid,
    ) -> QueueResult<bool> {
        // CQL deletes do not report presence; read first.
        let present = self
            .select_pointer(kind, queue, region, shard_id, queue_message_id)
            .await?
            .is_some();
        if !present {
            return Ok(false);
        }
        self.session
            .execute(
                self.pointer_stmt(kind, PointerOp::Delete),
                (queue, region, shard_id, CqlTimeuuid::from(queue_message_id)),
            )
            .await
            .map_err(QueueError::storage)?;
        Ok(true)
    }

    async fn scan_pointers(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
        after: Option<Uuid>,
        limit: usize,
    ) -> QueueResult<Vec<QueueMessageRow>> {
        let limit = limit as i32;
        let result = match after {
            Some(cursor) => {
                self.session
                    .execute(
                        self.pointer_stmt(kind, PointerOp::ScanAfter),
                        (queue, region, shard_id, CqlTimeuuid::from(cursor), limit),
                    )
                    .await
            }
            None => {
                self.session
                    .execute(
                        self.pointer_stmt(kind, PointerOp::Scan),
                        (queue, region, shard_id, limit),
                    )
                    .await
            }
        }
        .map_err(QueueError::storage)?;

        result
            .rows_typed_or_empty::<(CqlTimeuuid, Uuid, i64, Option<i64>)>()
            .map(|row| {
                row.map(
                    |(queue_message_id, message_id, queued_at, inflight_at)| QueueMessageRow {
                        queue: queue.to_string(),
                        region: region.to_string(),
                        shard_id,
                        queue_message_id: Uuid::from(queue_message_id),
                        message_id,
                        queued_at,
                        inflight_at,
                    },
                )
                .map_err(QueueError::storage)
            })
            .collect()
    }

    async fn delete_pointers(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
    ) -> QueueResult<()> {
        self.session
            .execute(
                self.pointer_stmt(kind, PointerOp::DeleteShard),
                (queue, region, shard_id),
            )
            .await
            .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn insert_body(&self, body: &MessageData) -> QueueResult<()> {
        self.session
            .execute(
                &self.stmts.insert_body,
                (
                    body.message_id,
                    body.content_type.as_str(),
                    body.data.to_vec(),
                ),
            )
            .await
            .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn select_body(&self, message_id: Uuid) -> QueueResult<Option<MessageData>> {
        let row = self
            .session
            .execute(&self.stmts.select_body, (message_id,))
            .await
            .map_err(QueueError::storage)?
            .maybe_first_row_typed::<(String, Vec<u8>)>()
            .map_err(QueueError::storage)?;
        Ok(row.map(|(content_type, data)| MessageData {
            message_id,
            content_type,
            data: data.into(),
        }))
    }

    async fn delete_body(&self, message_id: Uuid) -> QueueResult<()> {
        self.session
            .execute(&self.stmts.delete_body, (message_id,))
            .await
            .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn scan_bodies(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> QueueResult<Vec<MessageData>> {
        let limit = limit as i32;
        let result = match after {
            Some(cursor) => {
                self.session
                    .execute(&self.stmts.scan_bodies_after, (cursor, limit))
                    .await
            }
            None => self.session.execute(&self.stmts.scan_bodies, (limit,)).await,
        }
        .map_err(QueueError::storage)?;

        result
            .rows_typed_or_empty::<(Uuid, String, Vec<u8>)>()
            .map(|row| {
                row.map(|(message_id, content_type, data)| MessageData {
                    message_id,
                    content_type,
                    data: data.into(),
                })
                .map_err(QueueError::storage)
            })
            .collect()
    }

    async fn add_counter(&self, key: &CounterKey, delta: i64) -> QueueResult<()> {
        self.session
            .execute(
                &self.stmts.update_counter,
                (
                    Counter(delta),
                    key.queue.as_str(),
                    key.region.as_str(),
                    key.kind.as_str(),
                    key.shard_id,
                ),
            )
            .await
            .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn read_counter(&self, key: &CounterKey) -> QueueResult<i64> {
        let row = self
            .session
            .execute(
                &self.stmts.select_counter,
                (
                    key.queue.as_str(),
                    key.region.as_str(),
                    key.kind.as_str(),
                    key.shard_id,
                ),
            )
            .await
            .map_err(QueueError::storage)?
            .maybe_first_row_typed::<(Counter,)>()
            .map_err(QueueError::storage)?;
        Ok(row.map(|(counter,)| counter.0).unwrap_or(0))
    }

    async fn delete_counters(&self, queue: &str, region: &str) -> QueueResult<()> {
        self.session
            .execute(&self.stmts.delete_counters, (queue, region))
            .await
            .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn append_audit(&self, row: &AuditLogRow) -> QueueResult<()> {
        self.session
            .execute(
                &self.stmts.insert_audit,
                (
                    row.message_id,
                    row.recorded_at,
                    row.action.as_str(),
                    row.queue.as_str(),
                    row.status.as_str(),
                    row.error.clone(),
                ),
            )
            .await
            .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn select_audit(&self, message_id: Uuid) -> QueueResult<Vec<AuditLogRow>> {
        self.session
            .execute(&self.stmts.select_audit, (message_id,))
            .await
            .map_err(QueueError::storage)?
            .rows_typed_or_empty::<(i64, String, String, String, Option<String>)>()
            .map(|row| {
                let (recorded_at, action, queue, status, error) =
                    row.map_err(QueueError::storage)?;
                Ok(AuditLogRow {
                    message_id,
                    recorded_at,
                    queue,
                    action: parse_audit_action(&action)?,
                    status: parse_audit_status(&status)?,
                    error,
                })
            })
            .collect()
    }
}
