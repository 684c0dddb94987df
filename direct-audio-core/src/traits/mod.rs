pub mod audio_host;
