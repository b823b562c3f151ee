pub mod http;
pub mod image;
pub mod logging;
pub mod telegram;
pub mod timing;
