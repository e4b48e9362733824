pub(crate) mod admitted_connection;
