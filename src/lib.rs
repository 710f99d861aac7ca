//! Slidenotes - Lecture Slide Summarization Service
//!
//! This crate turns uploaded lecture slides into Markdown notes using a
//! third-party generative-AI provider. Every provider call passes through an
//! admission pipeline that enforces one in-flight job per client, a durable
//! per-day quota and a per-minute rate window.

pub mod admission;
pub mod config;
pub mod error;
pub mod files;
pub mod http;
pub mod provider;
pub mod store;
