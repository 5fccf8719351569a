//! Ledger Bot Library
//!
//! A Telegram bot that keeps a small team's money in order.
//!
//! This crate provides the core functionality for:
//! - Loading settings and the role roster from the environment
//! - Tracking balances, transactions and expense claims (Supabase or memory)
//! - Driving per-user dialogues from messages and inline buttons
//! - Receiving updates by long polling or through a webhook

pub mod commands;
pub mod config;
pub mod dialogue;
pub mod ledger;
pub mod telegram;
pub mod transport;
