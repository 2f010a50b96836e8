pub mod file_job_store;
pub mod memory_job_store;
