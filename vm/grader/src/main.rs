//! Runs every grader test case and reports the result.

use vm_grader::*;

fn main() {
    let ok = TestDriver::start([
        // Frame table.
        &frame_table::record_and_lookup,
        &frame_table::record_replaces,
        &frame_table::release,
        &frame_table::release_unowned_panics,
        &frame_table::lookups_are_read_only,
        &frame_table::frames_of_process,
        // Supplemental page table.
        &spt::insert_lazy,
        &spt::insert_resident,
        &spt::insert_overwrites,
        &spt::lookup_unaligned,
        &spt::clear,
        &spt::clear_missing_panics,
        &spt::remove,
        &spt::per_process_keys,
        // Swap.
        &swap::geometry,
        &swap::write_out_layout,
        &swap::round_trip,
        &swap::unused_slots_first,
        &swap::reuse_lowest_free,
        &swap::exhaustion,
        &swap::write_error_consumes_nothing,
        &swap::read_error_keeps_slot,
        &swap::release_all,
        &swap::duplicate_owner_panics,
        // Eviction policies.
        &eviction::fifo_order,
        &eviction::fifo_reinsert,
        &eviction::fifo_release,
        &eviction::fifo_reinstate,
        &eviction::clock_second_chance,
        &eviction::clock_all_accessed,
        // Page faults.
        &fault::null_address,
        &fault::kernel_address,
        &fault::guard_page,
        &fault::stack_margin,
        &fault::stack_above_sp,
        &fault::stack_grows_down,
        &fault::stack_limit,
        &fault::guard_page_allowed,
        &fault::unbacked,
        &fault::mapped_page_faults_again,
        &fault::write_to_read_only,
        &fault::error_code,
        &fault::kill_releases_memory,
        &fault::swap_exhaustion_kills,
        &fault::register_errors,
        &fault::process_errors,
        &fault::fault_after_exit,
        // Scenarios.
        &scenario::lazy_load_code,
        &scenario::evict_oldest,
        &scenario::swap_in,
        &scenario::exit_frees_swap,
        &scenario::cross_page_access,
        &scenario::mmap_write_back,
        &scenario::mmap_write_back_swapped,
        &scenario::mmap_clean_pages,
        &scenario::exit_writes_back,
        &scenario::read_only_swap,
        &scenario::mmap_lost_write_back,
        // Concurrency.
        &concurrency::disjoint_processes,
        &concurrency::exit_while_faulting,
    ]);
    if !ok {
        std::process::exit(1);
    }
}
