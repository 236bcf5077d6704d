mod channel;
mod net_time_checker;
mod orphan;
mod util;
