use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Initializes the Snowflake generator. `machine_id` and `node_id` are each
/// in 0-31; call once at process start so concurrent binaries on the same
/// host do not collide.
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = ID_GENERATOR.lock().unwrap();
    *gen = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Returns the next unique id as a decimal string.
pub fn next_id() -> String {
    let mut gen = ID_GENERATOR.lock().unwrap();
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}

/// Server-minted session token handed back at registration.
pub fn session_id() -> String {
    format!("sess-{}", next_id())
}

/// Identifier for a materialized alert.
pub fn alert_id() -> String {
    format!("alert-{}", next_id())
}
