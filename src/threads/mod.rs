pub mod async_build;
