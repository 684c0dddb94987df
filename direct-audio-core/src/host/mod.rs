pub mod virtual_host;
