#![allow(dead_code)]

mod server;

pub use server::{TestClient, TestServer, ADMIN_TOKEN};
