/* This file is part of coretune
 *
 * Copyright (C) 2023-2026 coretune developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

pub mod stoppable_task;
pub use stoppable_task::{StoppableTask, StoppableTaskPtr};

use std::sync::Arc;

pub type ExecutorPtr = Arc<smol::Executor<'static>>;

pub async fn sleep(seconds: u64) {
    smol::Timer::after(std::time::Duration::from_secs(seconds)).await;
}

pub async fn msleep(millis: u64) {
    smol::Timer::after(std::time::Duration::from_millis(millis)).await;
}
