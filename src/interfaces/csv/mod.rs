pub mod message_reader;
pub mod result_writer;
