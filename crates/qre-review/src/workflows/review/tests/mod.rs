mod common;
mod evidence;
mod reprocessing;
