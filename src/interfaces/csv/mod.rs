//! CSV surface of the `namepay` binary: operations in, payment book out.

pub mod operation_reader;
pub mod payment_writer;
pub mod replay;
