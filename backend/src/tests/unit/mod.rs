mod pauses;
mod tasks;
