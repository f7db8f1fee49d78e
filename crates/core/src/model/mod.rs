pub mod action;
pub mod command;
pub mod container;
pub mod interactive;
pub mod objects;
