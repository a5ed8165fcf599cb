pub mod instance_management;
pub mod message_dispatch;
