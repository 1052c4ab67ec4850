#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classification;
pub mod config;
pub mod dataset;
pub mod decision;
pub mod evaluation;
pub mod observability;
pub mod pipeline;
pub mod util;
