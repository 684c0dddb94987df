pub mod device_registry;
