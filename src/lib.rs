#![allow(async_fn_in_trait)]

pub mod crypto;
pub mod extractors;
pub mod hls;
pub mod http;
pub mod jsunpack;
pub mod preference;
