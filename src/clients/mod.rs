pub mod compile_client;
