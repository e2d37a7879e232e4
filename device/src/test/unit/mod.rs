mod buffer;
mod config;
mod device;
