mod by_the_book_tests;
mod common;
mod on_the_fly_tests;
