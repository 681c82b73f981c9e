//! Host-based tests for the ESP32 HTTP updater
//! These tests run on the development machine, not on the ESP32

pub mod fakes;

#[cfg(test)]
mod scenarios;
