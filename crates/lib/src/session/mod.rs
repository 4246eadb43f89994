//! Cook sessions: the loops that drive the executor to completion.

pub mod by_the_book;
pub mod on_the_fly;

pub use by_the_book::{
  ByTheBookOptions, collect_files_to_cook, finish_cook_by_the_book, run_cook_by_the_book, start_cook_by_the_book,
};
pub use on_the_fly::{run_cook_on_the_fly, start_cook_on_the_fly};
