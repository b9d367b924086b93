mod client;
mod jobs;
mod types;

pub use client::{ClientOptions, GitLabClient};
