/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! otaflow is primarily an application. The library target exists so that the
//! interactive flow and its collaborators can be exercised from integration
//! tests. All Rust APIs can change at any time.

pub mod adb;
pub mod cli;
pub mod config;
pub mod download;
pub mod keys;
pub mod patch;
pub mod selection;
pub mod store;
pub mod tool;
