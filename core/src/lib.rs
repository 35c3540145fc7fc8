// Copyright (c) 2026 Wardrobe Contributors. MIT License.
// See LICENSE for details.

//! # Wardrobe: Core Library
//!
//! The data layer of a second-hand clothing marketplace. Users list items,
//! and buyers carry a purchase from initiation to delivery through a short,
//! strictly ordered lifecycle. This crate owns the records and their rules;
//! the `wardrobe-engine` crate decides who may do what, and when.
//!
//! ## Architecture
//!
//! - **transaction**: The purchase record and its forward-only state machine.
//! - **identity**: Signed session tokens. Who is calling, and until when.
//! - **artifact**: Content-addressed storage for uploaded payment proofs.
//! - **notify**: Best-effort mail and chat side effects.
//! - **storage**: sled persistence with atomic multi-tree commits.
//! - **config**: Limits, defaults and format constants.
//!
//! ## Design Philosophy
//!
//! 1. State only moves forward. There is no code path that rewinds a record.
//! 2. The seller is never stored on a transaction; it is always the listing's
//!    owner.
//! 3. Side effects that can fail quietly (mail, chat) are never allowed to
//!    block the ones that cannot (state, availability).

pub mod artifact;
pub mod config;
pub mod identity;
pub mod notify;
pub mod storage;
pub mod transaction;
