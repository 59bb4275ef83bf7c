use strum::{Display, EnumString};

/// Transaction isolation levels, displayed and parsed by their SQL names.
#[derive(Display, EnumString, Debug, Clone, Copy, Eq, PartialEq)]
#[strum(ascii_case_insensitive)]
pub enum IsolationLevel {
    #[strum(serialize = "READ UNCOMMITTED")]
    ReadUncommitted,
    #[strum(serialize = "READ COMMITTED")]
    ReadCommitted,
    #[strum(serialize = "REPEATABLE READ")]
    RepeatableRead,
    #[strum(serialize = "SERIALIZABLE")]
    Serializable,
}

impl IsolationLevel {
    /// The statement that applies this level to the next transaction on the connection.
    pub fn set_statement(&self) -> String {
        format!("SET TRANSACTION ISOLATION LEVEL {}", self)
    }
}
