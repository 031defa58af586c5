#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("column `{column}` is not part of the {table} schema")]
    UnknownColumn { table: &'static str, column: String },
    #[error("unknown meter family `{0}` in stored row")]
    UnknownFamily(String),
    #[error("energy counter {0} does not fit the store's integer range")]
    CounterOutOfRange(u64),
    #[error("local UTC offset of {0} s is out of range")]
    OffsetOutOfRange(i64),
}
