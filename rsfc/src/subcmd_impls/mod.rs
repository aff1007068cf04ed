pub mod args;
mod common;
mod connectivity;
mod export;
mod network;
mod pipeline;
mod plot;
mod preprocess;
mod register;
mod utils;
