extern crate serde;
extern crate toml;

pub mod aligner;
pub mod communications;
pub mod configs;
pub mod error;
pub mod grid;
pub mod hardware;
pub mod interpolate;
pub mod laser;
pub mod maxima;
pub mod scan;
pub mod sim;
pub mod util;
