pub mod store_file;
