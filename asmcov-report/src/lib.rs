// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

pub mod listing;
pub mod report;

pub use listing::{Entry, Listing};
pub use report::{Report, ReportLine, Summary};
