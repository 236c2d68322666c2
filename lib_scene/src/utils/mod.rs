/// Reads process and system memory usage from procfs.
pub mod sys_info;
