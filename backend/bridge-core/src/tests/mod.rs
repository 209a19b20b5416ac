mod codec;
mod frame;
mod queue;
mod wire;
