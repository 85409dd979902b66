pub mod actor;
pub mod courier;
pub mod dish;
pub mod invoice;
pub mod notification;
pub mod order;
