pub mod image_sequence_reader;
pub mod image_sequence_writer;
pub mod threaded_frame_sink;
