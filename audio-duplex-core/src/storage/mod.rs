pub mod wav_dump;
