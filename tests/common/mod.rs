#![allow(dead_code)]

pub mod data_generators;
pub mod file_builder;
