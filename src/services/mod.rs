pub mod acknowledgement;
pub mod concentrator;
pub mod dispatch;
pub mod notifications;
pub mod poller;
pub mod templates;
