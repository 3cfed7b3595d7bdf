mod fake_server;
mod integration;
