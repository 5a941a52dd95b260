/// Per frame phases of a simulation. Fixed rate movement always commits
/// before the post physics phase reads it.
pub trait TickPhases {
    fn step_variable_rate(&mut self, dt: f32);
    fn step_fixed_rate(&mut self, fixed_dt: f32);
    fn step_post_physics(&mut self, dt: f32);
}

/// Accumulator that turns variable frame times into fixed ticks.
#[derive(Debug, Clone)]
pub struct FixedStepper {
    fixed_delta: f64,
    accumulator: f64,
    max_steps_per_frame: u32,
    time: f64,
    fixed_ticks: u64,
}

impl FixedStepper {
    pub fn new(fixed_delta: f32) -> Self {
        Self {
            fixed_delta: fixed_delta as f64,
            accumulator: 0.0,
            max_steps_per_frame: 8,
            time: 0.0,
            fixed_ticks: 0,
        }
    }

    pub fn with_max_steps(mut self, max_steps_per_frame: u32) -> Self {
        self.max_steps_per_frame = max_steps_per_frame.max(1);
        self
    }

    /// Simulation time advanced in fixed steps.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn fixed_ticks(&self) -> u64 {
        self.fixed_ticks
    }

    pub fn fixed_delta(&self) -> f32 {
        self.fixed_delta as f32
    }

    /// Runs one frame: variable rate, as many fixed ticks as are due, then
    /// post physics. Returns the number of fixed ticks run.
    pub fn advance<T: TickPhases>(&mut self, target: &mut T, frame_dt: f32) -> u32 {
        target.step_variable_rate(frame_dt);

        self.accumulator += frame_dt.max(0.0) as f64;
        let mut steps = 0;
        while self.accumulator + 1e-9 >= self.fixed_delta && steps < self.max_steps_per_frame {
            target.step_fixed_rate(self.fixed_delta as f32);
            self.accumulator -= self.fixed_delta;
            self.time += self.fixed_delta;
            self.fixed_ticks += 1;
            steps += 1;
        }
        // a long stall is dropped instead of replayed
        if steps == self.max_steps_per_frame {
            self.accumulator = self.accumulator.min(self.fixed_delta);
        }

        target.step_post_physics(frame_dt);
        steps
    }
}
