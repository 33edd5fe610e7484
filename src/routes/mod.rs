pub mod audit;
pub mod certificates;
pub mod documents;
pub mod web;
