pub mod vimeo;

pub use vimeo::VimeoClient;
