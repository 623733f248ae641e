pub mod bus;
pub mod messages;
pub mod protocol;
