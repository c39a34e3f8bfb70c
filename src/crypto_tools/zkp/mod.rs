pub mod chaum_pedersen;
