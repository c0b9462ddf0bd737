// SPDX-License-Identifier: GPL-3.0-or-later

pub mod args;
pub mod config;
pub mod detectors;
pub mod dispatch;
pub mod ingress;
pub mod patch;
pub mod protocol;
pub mod receiver;
