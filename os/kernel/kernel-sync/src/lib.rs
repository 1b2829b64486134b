//! # Kernel synchronization primitives
//!
//! The memory manager is only ever driven from one logical thread of control,
//! but its global handle still sits behind a [`SpinLock`] so that every
//! operation runs as one scoped critical section whose release is tied to
//! the guard, including early returns and unwinding.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
