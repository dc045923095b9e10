//! Machine layer for the virtual-memory subsystem.
//!
//! This crate provides the low-level building blocks that the virtual-memory
//! core sits on: typed addresses, the page-fault error code reported by the
//! trap layer, the spinlock used as the global virtual-memory lock, kernel
//! logging, block devices, and the physical page allocator.
//!
//! Everything here is a leaf collaborator. None of these types know about
//! processes, page tables, or swap; they only move bytes and hand out
//! frames.
#![no_std]
#![allow(clippy::new_without_default)]

extern crate alloc;

pub mod addressing;
pub mod dev;
pub mod interrupt;
pub mod kprint;
pub mod mm;
pub mod spinlock;

pub use kprint::QUIET;
