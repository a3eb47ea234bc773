//! Protocol adapters binding the query and procedure step core to a transport

pub mod dimse;
