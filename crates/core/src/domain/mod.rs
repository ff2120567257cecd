pub mod catalog;
pub mod conversation;
pub mod customer;
pub mod job;
