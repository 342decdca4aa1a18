pub mod container;
pub mod frame_file;
pub mod image_io;
