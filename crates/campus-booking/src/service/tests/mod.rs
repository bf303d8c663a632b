mod common;
mod routing;
mod workflow;
