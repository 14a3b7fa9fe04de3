//! Example MapReduce applications, kept outside the engine: a workload is
//! just a pair of plain functions matching [`common::MapFn`] and
//! [`common::ReduceFn`].

pub mod wc;
