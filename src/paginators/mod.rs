//! Stock pagination strategies
//!
//! Each paginator implements [`Paginator`](crate::operations::Paginator) for
//! any page type that exposes the fields it needs through a small trait.

mod scroll;
mod token;
mod windowed;

pub use scroll::{ScrollPage, ScrollPaginator};
pub use token::{QueryParams, TokenPage, TokenPaginator, TokenParams};
pub use windowed::{WindowProgress, WindowedPage, WindowedPaginator};
