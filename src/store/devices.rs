//! PLC device and tag definition CRUD (§3 PlcDevice/TagDefinition, §4.2
//! query surface). Every upsert records an audit row in the same
//! transaction as the mutation.

use crate::error::Result;
use crate::store::audit;
use crate::store::schema::{AuditAction, AuditSource, PlcDeviceRow, PlcStatus, TagDefinitionRow};
use crate::store::Store;
use rusqlite::{params, OptionalExtension, Row, Transaction};

fn row_to_device(row: &Row) -> rusqlite::Result<PlcDeviceRow> {
    let connection_config: String = row.get("connection_config")?;
    let stats: String = row.get("stats")?;
    let status: String = row.get("status")?;
    let protocol: String = row.get("protocol")?;
    Ok(PlcDeviceRow {
        id: row.get("id")?,
        name: row.get("name")?,
        protocol: protocol.parse().unwrap_or(crate::store::schema::Protocol::Opcua),
        enabled: row.get::<_, i64>("enabled")? != 0,
        connection_config: serde_json::from_str(&connection_config).unwrap_or(serde_json::Value::Null),
        scan_interval_ms: row.get::<_, i64>("scan_interval_ms")? as u64,
        timeout_ms: row.get::<_, i64>("timeout_ms")? as u64,
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        status: status.parse().unwrap_or(PlcStatus::Disconnected),
        last_connect_time: row.get("last_connect_time")?,
        last_error: row.get("last_error")?,
        stats: serde_json::from_str(&stats).unwrap_or(serde_json::Value::Null),
        portal_sync: row.get::<_, i64>("portal_sync")? != 0,
        local_only: row.get::<_, i64>("local_only")? != 0,
    })
}

fn row_to_tag(row: &Row) -> rusqlite::Result<TagDefinitionRow> {
    let data_type: String = row.get("data_type")?;
    let alarm_config: Option<String> = row.get("alarm_config")?;
    Ok(TagDefinitionRow {
        id: row.get("id")?,
        plc_id: row.get("plc_id")?,
        name: row.get("name")?,
        address: row.get("address")?,
        data_type: data_type.parse().unwrap_or(crate::store::schema::DataType::Float64),
        scan_class: row.get("scan_class")?,
        active: row.get::<_, i64>("active")? != 0,
        unit: row.get("unit")?,
        scaling_enabled: row.get::<_, i64>("scaling_enabled")? != 0,
        scaling_factor: row.get("scaling_factor")?,
        scaling_offset: row.get("scaling_offset")?,
        min_value: row.get("min_value")?,
        max_value: row.get("max_value")?,
        deadband: row.get("deadband")?,
        log_enabled: row.get::<_, i64>("log_enabled")? != 0,
        alarm_enabled: row.get::<_, i64>("alarm_enabled")? != 0,
        alarm_config: alarm_config.and_then(|s| serde_json::from_str(&s).ok()),
        last_value: row.get("last_value")?,
        last_quality: row.get::<_, Option<i64>>("last_quality")?.map(|v| v as u8),
        last_timestamp: row.get("last_timestamp")?,
        portal_sync: row.get::<_, i64>("portal_sync")? != 0,
        local_only: row.get::<_, i64>("local_only")? != 0,
    })
}

fn fetch_device(tx: &Transaction, id: &str) -> rusqlite::Result<Option<PlcDeviceRow>> {
    tx.query_row(
        "SELECT id, name, protocol, enabled, connection_config, scan_interval_ms, timeout_ms,
                retry_count, status, last_connect_time, last_error, stats, portal_sync, local_only
         FROM plc_devices WHERE id = ?1",
        [id],
        row_to_device,
    )
    .optional()
}

fn fetch_tag(tx: &Transaction, id: &str) -> rusqlite::Result<Option<TagDefinitionRow>> {
    tx.query_row(
        "SELECT id, plc_id, name, address, data_type, scan_class, active, unit, scaling_enabled,
                scaling_factor, scaling_offset, min_value, max_value, deadband, log_enabled,
                alarm_enabled, alarm_config, last_value, last_quality, last_timestamp, portal_sync, local_only
         FROM tag_definitions WHERE id = ?1",
        [id],
        row_to_tag,
    )
    .optional()
}

impl Store {
    /// Upserts a PLC device's identity/config fields (not its runtime
    /// status, which `update_device_status` owns). Emits an audit record.
    pub async fn upsert_device(
        &self,
        device: PlcDeviceRow,
        source: AuditSource,
        now_ms: i64,
    ) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let prior = fetch_device(&tx, &device.id)?;
            let action = if prior.is_some() {
                AuditAction::Update
            } else {
                AuditAction::Create
            };
            tx.execute(
                "INSERT INTO plc_devices (id, name, protocol, enabled, connection_config,
                    scan_interval_ms, timeout_ms, retry_count, portal_sync, local_only)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    protocol = excluded.protocol,
                    enabled = excluded.enabled,
                    connection_config = excluded.connection_config,
                    scan_interval_ms = excluded.scan_interval_ms,
                    timeout_ms = excluded.timeout_ms,
                    retry_count = excluded.retry_count,
                    portal_sync = excluded.portal_sync,
                    local_only = excluded.local_only",
                params![
                    device.id,
                    device.name,
                    device.protocol.as_str(),
                    device.enabled as i64,
                    device.connection_config.to_string(),
                    device.scan_interval_ms as i64,
                    device.timeout_ms as i64,
                    device.retry_count as i64,
                    device.portal_sync as i64,
                    device.local_only as i64,
                ],
            )?;
            let new_json = serde_json::to_value(&device).ok();
            let prior_json = prior.and_then(|p| serde_json::to_value(p).ok());
            audit::insert(
                &tx,
                "plc_device",
                &device.id,
                action,
                prior_json.as_ref(),
                new_json.as_ref(),
                source,
                now_ms,
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_tag(
        &self,
        tag: TagDefinitionRow,
        source: AuditSource,
        now_ms: i64,
    ) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let prior = fetch_tag(&tx, &tag.id)?;
            let action = if prior.is_some() {
                AuditAction::Update
            } else {
                AuditAction::Create
            };
            tx.execute(
                "INSERT INTO tag_definitions (id, plc_id, name, address, data_type, scan_class,
                    active, unit, scaling_enabled, scaling_factor, scaling_offset, min_value,
                    max_value, deadband, log_enabled, alarm_enabled, alarm_config, portal_sync, local_only)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                 ON CONFLICT(id) DO UPDATE SET
                    plc_id = excluded.plc_id,
                    name = excluded.name,
                    address = excluded.address,
                    data_type = excluded.data_type,
                    scan_class = excluded.scan_class,
                    active = excluded.active,
                    unit = excluded.unit,
                    scaling_enabled = excluded.scaling_enabled,
                    scaling_factor = excluded.scaling_factor,
                    scaling_offset = excluded.scaling_offset,
                    min_value = excluded.min_value,
                    max_value = excluded.max_value,
                    deadband = excluded.deadband,
                    log_enabled = excluded.log_enabled,
                    alarm_enabled = excluded.alarm_enabled,
                    alarm_config = excluded.alarm_config,
                    portal_sync = excluded.portal_sync,
                    local_only = excluded.local_only",
                params![
                    tag.id,
                    tag.plc_id,
                    tag.name,
                    tag.address,
                    tag.data_type.to_string(),
                    tag.scan_class,
                    tag.active as i64,
                    tag.unit,
                    tag.scaling_enabled as i64,
                    tag.scaling_factor,
                    tag.scaling_offset,
                    tag.min_value,
                    tag.max_value,
                    tag.deadband,
                    tag.log_enabled as i64,
                    tag.alarm_enabled as i64,
                    tag.alarm_config.as_ref().map(|v| v.to_string()),
                    tag.portal_sync as i64,
                    tag.local_only as i64,
                ],
            )?;
            let new_json = serde_json::to_value(&tag).ok();
            let prior_json = prior.and_then(|p| serde_json::to_value(p).ok());
            audit::insert(
                &tx,
                "tag_definition",
                &tag.id,
                action,
                prior_json.as_ref(),
                new_json.as_ref(),
                source,
                now_ms,
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn list_devices(&self, enabled_only: bool) -> Result<Vec<PlcDeviceRow>> {
        self.with_conn(move |conn| {
            let sql = if enabled_only {
                "SELECT id, name, protocol, enabled, connection_config, scan_interval_ms, timeout_ms,
                        retry_count, status, last_connect_time, last_error, stats, portal_sync, local_only
                 FROM plc_devices WHERE enabled = 1"
            } else {
                "SELECT id, name, protocol, enabled, connection_config, scan_interval_ms, timeout_ms,
                        retry_count, status, last_connect_time, last_error, stats, portal_sync, local_only
                 FROM plc_devices"
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([], row_to_device)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn get_device(&self, id: &str) -> Result<Option<PlcDeviceRow>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name, protocol, enabled, connection_config, scan_interval_ms, timeout_ms,
                        retry_count, status, last_connect_time, last_error, stats, portal_sync, local_only
                 FROM plc_devices WHERE id = ?1",
                [&id],
                row_to_device,
            )
            .optional()
        })
        .await
    }

    /// `device_id = None` lists tags for every device.
    pub async fn list_tags(&self, device_id: Option<&str>, active_only: bool) -> Result<Vec<TagDefinitionRow>> {
        let device_id = device_id.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let (sql, clamp_device) = match (&device_id, active_only) {
                (Some(_), true) => (
                    "SELECT id, plc_id, name, address, data_type, scan_class, active, unit, scaling_enabled,
                            scaling_factor, scaling_offset, min_value, max_value, deadband, log_enabled,
                            alarm_enabled, alarm_config, last_value, last_quality, last_timestamp, portal_sync, local_only
                     FROM tag_definitions WHERE plc_id = ?1 AND active = 1",
                    true,
                ),
                (Some(_), false) => (
                    "SELECT id, plc_id, name, address, data_type, scan_class, active, unit, scaling_enabled,
                            scaling_factor, scaling_offset, min_value, max_value, deadband, log_enabled,
                            alarm_enabled, alarm_config, last_value, last_quality, last_timestamp, portal_sync, local_only
                     FROM tag_definitions WHERE plc_id = ?1",
                    true,
                ),
                (None, true) => (
                    "SELECT id, plc_id, name, address, data_type, scan_class, active, unit, scaling_enabled,
                            scaling_factor, scaling_offset, min_value, max_value, deadband, log_enabled,
                            alarm_enabled, alarm_config, last_value, last_quality, last_timestamp, portal_sync, local_only
                     FROM tag_definitions WHERE active = 1",
                    false,
                ),
                (None, false) => (
                    "SELECT id, plc_id, name, address, data_type, scan_class, active, unit, scaling_enabled,
                            scaling_factor, scaling_offset, min_value, max_value, deadband, log_enabled,
                            alarm_enabled, alarm_config, last_value, last_quality, last_timestamp, portal_sync, local_only
                     FROM tag_definitions",
                    false,
                ),
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = if clamp_device {
                stmt.query_map([device_id.as_ref().unwrap()], row_to_tag)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            } else {
                stmt.query_map([], row_to_tag)?.collect::<rusqlite::Result<Vec<_>>>()?
            };
            Ok(rows)
        })
        .await
    }

    pub async fn update_device_status(
        &self,
        id: &str,
        status: PlcStatus,
        last_connect_time: Option<i64>,
        last_error: Option<String>,
    ) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE plc_devices SET status = ?1, last_connect_time = COALESCE(?2, last_connect_time),
                    last_error = ?3 WHERE id = ?4",
                params![status.to_string(), last_connect_time, last_error, id],
            )?;
            Ok(())
        })
        .await
    }

    /// Updates a tag's cached last-value/quality/timestamp and, when
    /// `log_enabled`, appends a row to `tag_history` (§4.2 query surface).
    pub async fn update_tag_value(
        &self,
        tag_id: &str,
        value: f64,
        quality: u8,
        timestamp_ms: i64,
        log_enabled: bool,
    ) -> Result<()> {
        let tag_id = tag_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE tag_definitions SET last_value = ?1, last_quality = ?2, last_timestamp = ?3 WHERE id = ?4",
                params![value, quality as i64, timestamp_ms, tag_id],
            )?;
            if log_enabled {
                tx.execute(
                    "INSERT INTO tag_history (tag_id, value, quality, timestamp) VALUES (?1, ?2, ?3, ?4)",
                    params![tag_id, value, quality as i64, timestamp_ms],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::{DataType, Protocol};

    fn sample_device(id: &str) -> PlcDeviceRow {
        PlcDeviceRow {
            id: id.to_string(),
            name: "Line 1 PLC".into(),
            protocol: Protocol::ModbusTcp,
            enabled: true,
            connection_config: serde_json::json!({"host": "10.0.0.5", "port": 502}),
            scan_interval_ms: 1000,
            timeout_ms: 3000,
            retry_count: 3,
            status: PlcStatus::Disconnected,
            last_connect_time: None,
            last_error: None,
            stats: serde_json::Value::Null,
            portal_sync: true,
            local_only: false,
        }
    }

    fn sample_tag(id: &str, plc_id: &str) -> TagDefinitionRow {
        TagDefinitionRow {
            id: id.to_string(),
            plc_id: plc_id.to_string(),
            name: "Temperature".into(),
            address: "40001".into(),
            data_type: DataType::Int16,
            scan_class: "default".into(),
            active: true,
            unit: Some("C".into()),
            scaling_enabled: false,
            scaling_factor: 1.0,
            scaling_offset: 0.0,
            min_value: None,
            max_value: None,
            deadband: None,
            log_enabled: true,
            alarm_enabled: false,
            alarm_config: None,
            last_value: None,
            last_quality: None,
            last_timestamp: None,
            portal_sync: true,
            local_only: false,
        }
    }

    #[tokio::test]
    async fn upsert_device_then_list() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_device(sample_device("plc-1"), AuditSource::Portal, 1000)
            .await
            .unwrap();
        let devices = store.list_devices(false).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "plc-1");
        assert_eq!(devices[0].protocol, Protocol::ModbusTcp);
    }

    #[tokio::test]
    async fn upsert_device_preserves_status_across_config_updates() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_device(sample_device("plc-1"), AuditSource::Portal, 1000)
            .await
            .unwrap();
        store
            .update_device_status("plc-1", PlcStatus::Connected, Some(2000), None)
            .await
            .unwrap();

        let mut updated = sample_device("plc-1");
        updated.name = "Line 1 PLC (renamed)".into();
        store.upsert_device(updated, AuditSource::Portal, 3000).await.unwrap();

        let device = store.get_device("plc-1").await.unwrap().unwrap();
        assert_eq!(device.name, "Line 1 PLC (renamed)");
        assert_eq!(device.status, PlcStatus::Connected);
    }

    #[tokio::test]
    async fn cascade_delete_removes_tags() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_device(sample_device("plc-1"), AuditSource::Local, 1000)
            .await
            .unwrap();
        store
            .upsert_tag(sample_tag("t-1", "plc-1"), AuditSource::Local, 1000)
            .await
            .unwrap();
        store
            .with_conn(|conn| conn.execute("DELETE FROM plc_devices WHERE id = 'plc-1'", []).map(|_| ()))
            .await
            .unwrap();
        let tags = store.list_tags(Some("plc-1"), false).await.unwrap();
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn update_tag_value_appends_history_when_log_enabled() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_device(sample_device("plc-1"), AuditSource::Local, 1000)
            .await
            .unwrap();
        store
            .upsert_tag(sample_tag("t-1", "plc-1"), AuditSource::Local, 1000)
            .await
            .unwrap();
        store.update_tag_value("t-1", 42.0, 192, 5000, true).await.unwrap();

        let tag = store
            .list_tags(Some("plc-1"), false)
            .await
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        assert_eq!(tag.last_value, Some(42.0));

        let history_count: i64 = store
            .with_conn(|conn| conn.query_row("SELECT count(*) FROM tag_history", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(history_count, 1);
    }
}
